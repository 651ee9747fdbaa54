//! Device-side LSD radix sort of `u32` keys, optionally carrying `u32` values.
//!
//! Every sort runs four 8-bit digit passes, least significant first. One pass
//! is recorded into one command encoder and submitted on its own:
//! - clear this pass' slice of the global histogram
//! - counting: per-partition digit counts (one workgroup per partition)
//! - prefix: per-partition destination offsets (one workgroup per digit)
//! - scatter: stable move from source to destination (one workgroup per partition)
//!
//! Source and destination swap between the caller's buffers and the engine's
//! scratch buffers every pass. Four is even, so the result always ends up in
//! the caller's buffers.

use crate::count::{DispatchGeometry, ElementCount};
use crate::error::SortError;
use crate::kernels::{KernelSet, ScatterVariant};
use crate::resources::{histogram_slice_offset, ResourcePlan, SortResources, HISTOGRAM_SLICE_BYTES};

/// Buckets per digit pass.
pub const RADIX: u32 = 256;
/// Key bits consumed per pass.
pub const RADIX_BITS: u32 = 8;
/// Digit passes per sort (32-bit keys).
pub const RADIX_PASSES: u32 = 4;
/// Threads per workgroup in every kernel.
pub const WORKGROUP_SIZE: u32 = 256;
/// Elements each thread covers in the counting and scatter phases.
pub const PARTITION_DIVISION: u32 = 8;
/// Elements one workgroup handles.
pub const PARTITION_SIZE: u32 = PARTITION_DIVISION * WORKGROUP_SIZE;

/// Construction options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SorterOptions {
    /// Use subgroup reductions in the prefix kernel. Needs [`wgpu::Features::SUBGROUP`].
    pub subgroups: bool,
}

/// Which side of the ping-pong is read and which is written in a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassRoles {
    /// Even pass: caller -> scratch
    CallerToScratch,
    /// Odd pass: scratch -> caller
    ScratchToCaller,
}

impl PassRoles {
    /// Roles of digit pass `pass`.
    pub fn of(pass: u32) -> Self {
        if pass % 2 == 0 { PassRoles::CallerToScratch } else { PassRoles::ScratchToCaller }
    }

    fn parity(self) -> usize {
        match self {
            PassRoles::CallerToScratch => 0,
            PassRoles::ScratchToCaller => 1,
        }
    }
}

/// Buffers of one sort call, borrowed for the duration of the call.
#[derive(Clone, Copy, Debug)]
pub struct SortRequest<'a> {
    /// Number of leading elements to sort
    pub count:  ElementCount<'a>,
    /// Keys, sorted in place
    pub keys:   &'a wgpu::Buffer,
    /// Values permuted along with the keys
    pub values: Option<&'a wgpu::Buffer>,
}

impl SortRequest<'_> {
    /// The scatter configuration a request with this shape runs with.
    pub fn variant(&self) -> ScatterVariant {
        match self.values {
            Some(_) => ScatterVariant::KeyValues,
            None    => ScatterVariant::KeysOnly,
        }
    }
}

/// Radix sort engine bound to one device and a fixed maximum capacity.
///
/// Internal buffers are allocated once and reused by every sort. Sorting only
/// records and submits work: the host never waits, and the caller must not
/// touch the sorted buffers until the queue has finished with them.
///
/// Every sort rewrites the engine's count, pass index and histograms, so the
/// entry points take `&mut self`. Threads that share one engine wrap it in a
/// `Mutex`; each sort then records and submits its four passes under the lock.
pub struct RadixSorter {
    device:        wgpu::Device,
    queue:         wgpu::Queue,
    kernels:       KernelSet,
    resources:     SortResources,
    storage_group: wgpu::BindGroup,
    uniform_group: wgpu::BindGroup,
}

impl RadixSorter {
    /// Engine able to sort up to `max_capacity` elements per call.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, max_capacity: u32) -> Result<Self, SortError> {
        Self::with_options(device, queue, max_capacity, SorterOptions::default())
    }

    /// Same as [`RadixSorter::new`], with explicit options.
    pub fn with_options(
        device:       &wgpu::Device,
        queue:        &wgpu::Queue,
        max_capacity: u32,
        options:      SorterOptions,
    ) -> Result<Self, SortError> {
        if options.subgroups && !device.features().contains(wgpu::Features::SUBGROUP) {
            return Err(SortError::MissingFeature("SUBGROUP"));
        }

        let kernels = KernelSet::build(device, options.subgroups)?;
        let resources = SortResources::allocate(device, ResourcePlan::new(max_capacity))?;

        let storage_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label:   Some("wrdx storage"),
            layout:  &kernels.storage_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: resources.element_count.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: resources.global_histogram.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: resources.partition_histogram.as_entire_binding() },
            ],
        });
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label:   Some("wrdx uniform"),
            layout:  &kernels.uniform_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: resources.sort_pass.as_entire_binding() },
            ],
        });

        log::info!("Radix sorter ready (capacity {}, options {:?})", max_capacity, options);

        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            kernels,
            resources,
            storage_group,
            uniform_group,
        })
    }

    /// Largest element count a sort may be asked for.
    pub fn max_capacity(&self) -> u32 {
        self.resources.plan.max_capacity
    }

    /// Partitions dispatched by a worst-case (indirect) sort.
    pub fn max_partitions(&self) -> u32 {
        self.resources.plan.partition_count
    }

    /// Sort the first `n` keys of `keys` in place.
    pub fn sort_keys(&mut self, n: u32, keys: &wgpu::Buffer) {
        self.sort(SortRequest { count: ElementCount::Host(n), keys, values: None });
    }

    /// Sort keys in place, reading the element count from `count` at
    /// `count_offset` on the device.
    pub fn sort_keys_indirect(&mut self, count: &wgpu::Buffer, count_offset: wgpu::BufferAddress, keys: &wgpu::Buffer) {
        self.sort(SortRequest {
            count:  ElementCount::Device { buffer: count, offset: count_offset },
            keys,
            values: None,
        });
    }

    /// Sort the first `n` keys in place, applying the same permutation to `values`.
    pub fn sort_key_values(&mut self, n: u32, keys: &wgpu::Buffer, values: &wgpu::Buffer) {
        self.sort(SortRequest { count: ElementCount::Host(n), keys, values: Some(values) });
    }

    /// Key-value sort with a device-resident element count.
    pub fn sort_key_values_indirect(
        &mut self,
        count:        &wgpu::Buffer,
        count_offset: wgpu::BufferAddress,
        keys:         &wgpu::Buffer,
        values:       &wgpu::Buffer,
    ) {
        self.sort(SortRequest {
            count:  ElementCount::Device { buffer: count, offset: count_offset },
            keys,
            values: Some(values),
        });
    }

    /// Record and submit the four digit passes of `request`.
    ///
    /// The element count must not exceed [`RadixSorter::max_capacity`] and the
    /// caller's buffers must hold at least that many `u32`s. Only host counts
    /// can be checked here, and only in debug builds.
    pub fn sort(&mut self, request: SortRequest<'_>) {
        let max_capacity = self.max_capacity();
        if let Some(n) = request.count.host_value() {
            debug_assert!(n <= max_capacity, "sorting {n} elements with a capacity of {max_capacity}");
            debug_assert!(request.keys.size() >= n as u64 * 4, "key buffer smaller than {n} elements");
            debug_assert!(
                request.values.map_or(true, |v| v.size() >= n as u64 * 4),
                "value buffer smaller than {n} elements",
            );
            if n == 0 {
                log::debug!("Empty sort request, nothing to do");
                return;
            }
        }

        let variant = request.variant();
        let geometry = request.count.geometry(max_capacity);
        log::debug!("Sorting ({:?}, {:?}) with {} partitions", variant, request.count.host_value(), geometry.partitions);

        let inout = self.inout_groups(&request);
        request.count.write_host(&self.queue, &self.resources.element_count);

        for pass in 0..RADIX_PASSES {
            // lands after the previous pass' submission, before this one
            self.queue.write_buffer(&self.resources.sort_pass, 0, bytemuck::bytes_of(&pass));

            let mut enc = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("wrdx digit pass"),
            });
            if pass == 0 {
                request.count.record_copy(&mut enc, &self.resources.element_count);
            }
            self.record_pass(&mut enc, pass, &inout[PassRoles::of(pass).parity()], variant, geometry);
            self.queue.submit([enc.finish()]);
            log::debug!("Digit pass {} submitted ({:?})", pass, PassRoles::of(pass));
        }
    }

    /// Release the engine's buffers immediately.
    pub fn destroy(self) {
        self.resources.destroy();
        log::debug!("Radix sorter destroyed");
    }

    #[cfg(test)]
    pub(crate) fn global_histogram(&self) -> &wgpu::Buffer {
        &self.resources.global_histogram
    }

    /// Clear -> counting -> prefix -> scatter of one digit pass.
    fn record_pass(
        &self,
        enc:      &mut wgpu::CommandEncoder,
        pass:     u32,
        inout:    &wgpu::BindGroup,
        variant:  ScatterVariant,
        geometry: DispatchGeometry,
    ) {
        enc.clear_buffer(&self.resources.global_histogram, histogram_slice_offset(pass), Some(HISTOGRAM_SLICE_BYTES));

        let phases = [
            ("wrdx counting", &self.kernels.counting, geometry.partitions),
            ("wrdx prefix", &self.kernels.prefix, geometry.digits),
            ("wrdx scatter", self.kernels.scatter(variant), geometry.partitions),
        ];
        // one compute pass per phase: each reads what the previous one wrote
        for (label, pipeline, workgroups) in phases {
            log::trace!("pass {pass}: {label} over {workgroups} workgroups");
            let mut cpass = enc.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label:            Some(label),
                timestamp_writes: None,
            });
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, &self.storage_group, &[]);
            cpass.set_bind_group(1, inout, &[]);
            cpass.set_bind_group(2, &self.uniform_group, &[]);
            cpass.dispatch_workgroups(workgroups, 1, 1);
        }
    }

    /// In/out bind groups of one call, indexed by pass parity.
    ///
    /// Built per call from the caller's buffers so the engine never keeps a
    /// reference to them.
    fn inout_groups(&self, request: &SortRequest<'_>) -> [wgpu::BindGroup; 2] {
        let res = &self.resources;
        let (values, scratch_values) = match request.values {
            Some(values) => (values, &res.scratch_values),
            None         => (&res.dummy, &res.dummy),
        };

        let mk = |label:      &str,
                  src_keys:   &wgpu::Buffer,
                  dst_keys:   &wgpu::Buffer,
                  src_values: &wgpu::Buffer,
                  dst_values: &wgpu::Buffer| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label:   Some(label),
                layout:  &self.kernels.inout_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: src_keys.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: dst_keys.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: src_values.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 3, resource: dst_values.as_entire_binding() },
                ],
            })
        };

        [
            mk("wrdx inout even", request.keys, &res.scratch_keys, values, scratch_values),
            mk("wrdx inout odd", &res.scratch_keys, request.keys, scratch_values, values),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu_utils::{create_storage_buffer, read_buffer_u32, request_device_blocking};

    use pretty_assertions::assert_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
        match request_device_blocking(wgpu::Features::empty()) {
            Ok(pair) => Some(pair),
            Err(err) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
        }
    }

    fn random_keys(rng: &mut ChaCha8Rng, n: usize) -> Vec<u32> {
        (0..n).map(|_| rng.gen()).collect()
    }

    fn gpu_sort_keys(device: &wgpu::Device, queue: &wgpu::Queue, sorter: &mut RadixSorter, keys: &[u32]) -> Vec<u32> {
        let buf = create_storage_buffer(device, "test keys", keys);
        sorter.sort_keys(keys.len() as u32, &buf);
        read_buffer_u32(device, queue, &buf, keys.len()).unwrap()
    }

    fn gpu_sort_pairs(
        device: &wgpu::Device,
        queue:  &wgpu::Queue,
        sorter: &mut RadixSorter,
        keys:   &[u32],
        values: &[u32],
    ) -> (Vec<u32>, Vec<u32>) {
        let kbuf = create_storage_buffer(device, "test keys", keys);
        let vbuf = create_storage_buffer(device, "test values", values);
        sorter.sort_key_values(keys.len() as u32, &kbuf, &vbuf);
        (
            read_buffer_u32(device, queue, &kbuf, keys.len()).unwrap(),
            read_buffer_u32(device, queue, &vbuf, values.len()).unwrap(),
        )
    }

    fn reference_sort_pairs(keys: &[u32], values: &[u32]) -> (Vec<u32>, Vec<u32>) {
        let mut pairs: Vec<(u32, u32)> = keys.iter().copied().zip(values.iter().copied()).collect();
        pairs.sort_by_key(|p| p.0);
        pairs.into_iter().unzip()
    }

    // stable counting sort on one digit, the host model of a single pass
    fn reference_pass(keys: &[u32], values: &[u32], pass: u32) -> (Vec<u32>, Vec<u32>) {
        let shift = pass * RADIX_BITS;
        let digit = |k: u32| ((k >> shift) & (RADIX - 1)) as usize;

        let mut offsets = [0usize; RADIX as usize];
        for &k in keys {
            offsets[digit(k)] += 1;
        }
        let mut sum = 0;
        for slot in offsets.iter_mut() {
            let count = *slot;
            *slot = sum;
            sum += count;
        }

        let mut out_keys = vec![0u32; keys.len()];
        let mut out_values = vec![0u32; values.len()];
        for (i, &k) in keys.iter().enumerate() {
            let dst = &mut offsets[digit(k)];
            out_keys[*dst] = k;
            if let Some(&v) = values.get(i) {
                out_values[*dst] = v;
            }
            *dst += 1;
        }
        (out_keys, out_values)
    }

    // ── host-only ────────────────────────────────────────────────────────────

    #[test]
    fn test_constants() {
        assert_eq!(PARTITION_SIZE, 2048);
        assert_eq!(RADIX, 1 << RADIX_BITS);
        assert_eq!(RADIX_PASSES * RADIX_BITS, 32);
    }

    #[test]
    fn test_pass_roles_return_to_caller() {
        let roles: Vec<PassRoles> = (0..RADIX_PASSES).map(PassRoles::of).collect();
        assert_eq!(roles, vec![
            PassRoles::CallerToScratch,
            PassRoles::ScratchToCaller,
            PassRoles::CallerToScratch,
            PassRoles::ScratchToCaller,
        ]);
        // the last pass writes into the caller's buffer
        assert_eq!(PassRoles::of(RADIX_PASSES - 1), PassRoles::ScratchToCaller);
    }

    #[test]
    fn test_reference_passes_sort() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let keys = random_keys(&mut rng, 10_000);
        let values: Vec<u32> = (0..keys.len() as u32).collect();

        let (mut k, mut v) = (keys.clone(), values.clone());
        for pass in 0..RADIX_PASSES {
            (k, v) = reference_pass(&k, &v, pass);
        }
        let (want_k, want_v) = reference_sort_pairs(&keys, &values);
        assert_eq!(k, want_k);
        assert_eq!(v, want_v);
    }

    // ── device ───────────────────────────────────────────────────────────────

    #[test]
    fn test_concrete_cases() {
        let Some((device, queue)) = test_device() else { return };
        let mut sorter = RadixSorter::new(&device, &queue, 16).unwrap();

        assert_eq!(gpu_sort_keys(&device, &queue, &mut sorter, &[5, 3, 8, 1]), vec![1, 3, 5, 8]);
        assert_eq!(gpu_sort_keys(&device, &queue, &mut sorter, &[0, 1, 3, 1]), vec![0, 1, 1, 3]);
        assert_eq!(
            gpu_sort_keys(&device, &queue, &mut sorter, &[u32::MAX, 0x0100_0000, 0xff, 0x0001_0000, 0]),
            vec![0, 0xff, 0x0001_0000, 0x0100_0000, u32::MAX],
        );
    }

    #[test]
    fn test_random_keys_match_reference() {
        let Some((device, queue)) = test_device() else { return };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut sorter = RadixSorter::new(&device, &queue, 100_000).unwrap();

        for n in [1usize, 255, 2048, 2049, 10_000, 99_999] {
            let keys = random_keys(&mut rng, n);
            let mut want = keys.clone();
            want.sort();
            assert_eq!(gpu_sort_keys(&device, &queue, &mut sorter, &keys), want, "n = {n}");
        }
    }

    #[test]
    fn test_million_keys_match_reference() {
        let Some((device, queue)) = test_device() else { return };
        let n = 1 << 20;
        let mut rng = ChaCha8Rng::seed_from_u64(1_048_576);
        let keys = random_keys(&mut rng, n);
        let values: Vec<u32> = (0..n as u32).collect();
        let mut sorter = RadixSorter::new(&device, &queue, n as u32).unwrap();

        let (got_k, got_v) = gpu_sort_pairs(&device, &queue, &mut sorter, &keys, &values);
        let (want_k, want_v) = reference_sort_pairs(&keys, &values);
        assert!(got_k == want_k, "keys differ from the reference sort");
        assert!(got_v == want_v, "values differ from the reference sort");
    }

    #[test]
    fn test_key_values_are_stable() {
        let Some((device, queue)) = test_device() else { return };
        let mut sorter = RadixSorter::new(&device, &queue, 1 << 14).unwrap();

        let (k, v) = gpu_sort_pairs(&device, &queue, &mut sorter, &[5, 3, 5, 3, 5], &[50, 30, 51, 31, 52]);
        assert_eq!(k, vec![3, 3, 5, 5, 5]);
        assert_eq!(v, vec![30, 31, 50, 51, 52]);

        // few distinct keys spread over several partitions
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let keys: Vec<u32> = (0..10_000).map(|_| rng.gen_range(0..16u32) << 12).collect();
        let values: Vec<u32> = (0..keys.len() as u32).collect();
        let got = gpu_sort_pairs(&device, &queue, &mut sorter, &keys, &values);
        assert_eq!(got, reference_sort_pairs(&keys, &values));
    }

    #[test]
    fn test_sorted_input_is_unchanged() {
        let Some((device, queue)) = test_device() else { return };
        let mut sorter = RadixSorter::new(&device, &queue, 8192).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut keys = random_keys(&mut rng, 8192);
        keys.sort();

        let once = gpu_sort_keys(&device, &queue, &mut sorter, &keys);
        assert_eq!(once, keys);
        assert_eq!(gpu_sort_keys(&device, &queue, &mut sorter, &once), keys);
    }

    #[test]
    fn test_indirect_matches_direct() {
        let Some((device, queue)) = test_device() else { return };
        let capacity = 20_000;
        let mut sorter = RadixSorter::new(&device, &queue, capacity).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        for n in [0usize, 1, 3000, 20_000] {
            let keys = random_keys(&mut rng, n);
            let values: Vec<u32> = (0..n as u32).rev().collect();

            let direct = gpu_sort_pairs(&device, &queue, &mut sorter, &keys, &values);

            let count = create_storage_buffer(&device, "test count", &[0xdead_beef, n as u32]);
            let worst_case = ElementCount::Device { buffer: &count, offset: 4 }.geometry(capacity);
            assert_eq!(worst_case.partitions, sorter.max_partitions());
            let kbuf = create_storage_buffer(&device, "test keys", &keys);
            let vbuf = create_storage_buffer(&device, "test values", &values);
            sorter.sort_key_values_indirect(&count, 4, &kbuf, &vbuf);
            let indirect = (
                read_buffer_u32(&device, &queue, &kbuf, n).unwrap(),
                read_buffer_u32(&device, &queue, &vbuf, n).unwrap(),
            );
            assert_eq!(indirect, direct, "n = {n}");

            let kbuf = create_storage_buffer(&device, "test keys", &keys);
            sorter.sort_keys_indirect(&count, 4, &kbuf);
            assert_eq!(read_buffer_u32(&device, &queue, &kbuf, n).unwrap(), direct.0, "n = {n}");
        }
    }

    #[test]
    fn test_tail_past_count_is_untouched() {
        let Some((device, queue)) = test_device() else { return };
        let mut sorter = RadixSorter::new(&device, &queue, 4096).unwrap();
        let mut keys: Vec<u32> = (0..3000u32).rev().collect();
        keys.extend(std::iter::repeat(7).take(1096));

        let kbuf = create_storage_buffer(&device, "test keys", &keys);
        sorter.sort_keys(3000, &kbuf);
        let got = read_buffer_u32(&device, &queue, &kbuf, keys.len()).unwrap();
        assert_eq!(&got[..3000], &(0..3000u32).collect::<Vec<_>>()[..]);
        assert!(got[3000..].iter().all(|&k| k == 7));

        let count = create_storage_buffer(&device, "test count", &[3000]);
        let kbuf = create_storage_buffer(&device, "test keys", &keys);
        sorter.sort_keys_indirect(&count, 0, &kbuf);
        assert_eq!(read_buffer_u32(&device, &queue, &kbuf, keys.len()).unwrap(), got);
    }

    #[test]
    fn test_empty_and_full_capacity() {
        let Some((device, queue)) = test_device() else { return };
        let capacity = 3 * PARTITION_SIZE + 17;
        let mut sorter = RadixSorter::new(&device, &queue, capacity).unwrap();
        assert_eq!(sorter.max_partitions(), 4);

        let kbuf = create_storage_buffer(&device, "test keys", &[9, 8, 7]);
        sorter.sort_keys(0, &kbuf);
        assert_eq!(read_buffer_u32(&device, &queue, &kbuf, 3).unwrap(), vec![9, 8, 7]);

        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let keys = random_keys(&mut rng, capacity as usize);
        let mut want = keys.clone();
        want.sort();
        assert_eq!(gpu_sort_keys(&device, &queue, &mut sorter, &keys), want);
    }

    #[test]
    fn test_engine_reuse_and_histogram_totals() {
        let Some((device, queue)) = test_device() else { return };
        let mut sorter = RadixSorter::new(&device, &queue, 50_000).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(8);

        for n in [50_000usize, 1234, 50_000] {
            let keys = random_keys(&mut rng, n);
            let mut want = keys.clone();
            want.sort();
            assert_eq!(gpu_sort_keys(&device, &queue, &mut sorter, &keys), want);

            let hist = read_buffer_u32(&device, &queue, sorter.global_histogram(), (RADIX * RADIX_PASSES) as usize).unwrap();
            for (pass, slice) in hist.chunks(RADIX as usize).enumerate() {
                assert_eq!(slice.iter().sum::<u32>(), n as u32, "pass {pass}");
            }
        }
        sorter.destroy();
    }

    #[test]
    fn test_sorts_need_exclusive_access() {
        fn assert_send<T: Send>() {}
        assert_send::<RadixSorter>();

        let _: fn(&mut RadixSorter, u32, &wgpu::Buffer) = RadixSorter::sort_keys;
        let _: fn(&mut RadixSorter, &wgpu::Buffer, wgpu::BufferAddress, &wgpu::Buffer) = RadixSorter::sort_keys_indirect;
        let _: fn(&mut RadixSorter, u32, &wgpu::Buffer, &wgpu::Buffer) = RadixSorter::sort_key_values;
        let _: fn(&mut RadixSorter, &wgpu::Buffer, wgpu::BufferAddress, &wgpu::Buffer, &wgpu::Buffer) =
            RadixSorter::sort_key_values_indirect;
        let _: fn(&mut RadixSorter, SortRequest<'_>) = RadixSorter::sort;
    }

    #[test]
    fn test_engine_shared_between_threads() {
        let Some((device, queue)) = test_device() else { return };
        let sorter = std::sync::Mutex::new(RadixSorter::new(&device, &queue, 50_000).unwrap());

        let wrong = std::thread::scope(|scope| {
            let workers: Vec<_> = [(50_000usize, 10u64), (3000, 11)]
                .into_iter()
                .map(|(n, seed)| {
                    let (device, queue, sorter) = (&device, &queue, &sorter);
                    scope.spawn(move || {
                        let mut rng = ChaCha8Rng::seed_from_u64(seed);
                        let mut wrong = 0;
                        for _ in 0..10 {
                            let keys = random_keys(&mut rng, n);
                            let mut want = keys.clone();
                            want.sort();
                            let kbuf = create_storage_buffer(device, "test keys", &keys);
                            sorter.lock().unwrap().sort_keys(n as u32, &kbuf);
                            if read_buffer_u32(device, queue, &kbuf, n).unwrap() != want {
                                wrong += 1;
                            }
                        }
                        wrong
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum::<usize>()
        });
        assert_eq!(wrong, 0);
    }

    #[test]
    fn test_capacity_beyond_limits_is_rejected() {
        let Some((device, queue)) = test_device() else { return };
        match RadixSorter::new(&device, &queue, u32::MAX) {
            Err(SortError::CapacityExceedsLimits { .. }) => {}
            Err(other) => panic!("expected a capacity error, got {other}"),
            Ok(_) => panic!("a sorter for u32::MAX elements should not fit any device"),
        }
    }

    #[test]
    fn test_subgroup_option() {
        let Ok((device, queue)) = request_device_blocking(wgpu::Features::SUBGROUP) else { return };
        let options = SorterOptions { subgroups: true };

        if !device.features().contains(wgpu::Features::SUBGROUP) {
            let res = RadixSorter::with_options(&device, &queue, 1024, options);
            assert!(matches!(res, Err(SortError::MissingFeature("SUBGROUP"))));
            return;
        }

        let mut sorter = RadixSorter::with_options(&device, &queue, 30_000, options).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let keys = random_keys(&mut rng, 30_000);
        let mut want = keys.clone();
        want.sort();
        assert_eq!(gpu_sort_keys(&device, &queue, &mut sorter, &keys), want);
    }
}
