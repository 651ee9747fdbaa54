//! Radix sort kernels: WGSL sources, conditional compilation, bind group
//! layouts and the compute pipelines built once per engine.

use crate::error::SortError;

const COMMON_SRC:  &str = include_str!("shaders/radix_common.wgsl");
const COUNT_SRC:   &str = include_str!("shaders/radix_count.wgsl");
const PREFIX_SRC:  &str = include_str!("shaders/radix_prefix.wgsl");
const SCATTER_SRC: &str = include_str!("shaders/radix_scatter.wgsl");

/// Flag that compiles payload propagation into the scatter kernel.
pub const KEY_VALUE_FLAG: &str = "KEY_VALUE";
/// Flag that switches the prefix kernel to subgroup reductions.
pub const SUBGROUPS_FLAG: &str = "SUBGROUPS";

/// Which scatter configuration a sort uses.
///
/// Both are compiled at construction; each entry point of the sorter is tied
/// to exactly one of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScatterVariant {
    /// Moves keys only; the payload slots are bound to a dummy buffer.
    KeysOnly,
    /// Moves each value together with its key.
    KeyValues,
}

impl ScatterVariant {
    /// Flags handed to the preprocessor for this variant.
    pub fn flags(self) -> &'static [&'static str] {
        match self {
            ScatterVariant::KeysOnly  => &[],
            ScatterVariant::KeyValues => &[KEY_VALUE_FLAG],
        }
    }
}

/// Resolve `#ifdef` / `#ifndef` / `#else` / `#endif` lines against `flags`.
///
/// Directive lines are dropped from the output, as are lines inside inactive
/// branches. Blocks nest.
pub fn preprocess(source: &str, flags: &[&str]) -> Result<String, SortError> {
    // one entry per open block: (block is active, an enclosing block is active)
    let mut stack: Vec<(bool, bool)> = Vec::new();
    let mut out = String::with_capacity(source.len());

    for (lineno, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        let enclosing = stack.last().map_or(true, |&(active, parent)| active && parent);

        if let Some(name) = trimmed.strip_prefix("#ifdef") {
            stack.push((flags.contains(&name.trim()), enclosing));
        } else if let Some(name) = trimmed.strip_prefix("#ifndef") {
            stack.push((!flags.contains(&name.trim()), enclosing));
        } else if trimmed.starts_with("#else") {
            match stack.last_mut() {
                Some(top) => top.0 = !top.0,
                None => return Err(SortError::KernelBuild(format!("line {}: #else without #ifdef", lineno + 1))),
            }
        } else if trimmed.starts_with("#endif") {
            if stack.pop().is_none() {
                return Err(SortError::KernelBuild(format!("line {}: #endif without #ifdef", lineno + 1)));
            }
        } else if enclosing {
            out.push_str(line);
            out.push('\n');
        }
    }

    if !stack.is_empty() {
        return Err(SortError::KernelBuild(format!("{} unterminated #ifdef block(s)", stack.len())));
    }
    Ok(out)
}

// ──────────────────────────────────────────────────────────────────────────────
// Layouts (must match the @group/@binding declarations in radix_common.wgsl)
// ──────────────────────────────────────────────────────────────────────────────

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty:         wgpu::BindingType::Buffer {
            ty:                 wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size:   None,
        },
        count:      None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty:         wgpu::BindingType::Buffer {
            ty:                 wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size:   None,
        },
        count:      None,
    }
}

/// Compiled kernels plus the layouts their bind groups are created from.
pub struct KernelSet {
    /// group 0: element count, global histogram, partition histogram
    pub storage_layout: wgpu::BindGroupLayout,
    /// group 1: source keys, destination keys, source values, destination values
    pub inout_layout:   wgpu::BindGroupLayout,
    /// group 2: pass index
    pub uniform_layout: wgpu::BindGroupLayout,
    /// Counting phase
    pub counting:       wgpu::ComputePipeline,
    /// Prefix phase
    pub prefix:         wgpu::ComputePipeline,
    scatter_keys:       wgpu::ComputePipeline,
    scatter_key_values: wgpu::ComputePipeline,
}

impl KernelSet {
    /// Compile every kernel. `subgroups` selects the subgroup prefix kernel;
    /// the caller checks the device feature beforehand.
    pub fn build(device: &wgpu::Device, subgroups: bool) -> Result<Self, SortError> {
        let storage_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label:   Some("wrdx storage layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                storage_entry(2, false),
            ],
        });
        // Both payload slots are writable so one dummy buffer can back them together.
        let inout_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label:   Some("wrdx inout layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                storage_entry(2, false),
                storage_entry(3, false),
            ],
        });
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label:   Some("wrdx uniform layout"),
            entries: &[uniform_entry(0)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label:                Some("wrdx pipeline layout"),
            bind_group_layouts:   &[&storage_layout, &inout_layout, &uniform_layout],
            push_constant_ranges: &[],
        });

        let prefix_flags: &[&str] = if subgroups { &[SUBGROUPS_FLAG] } else { &[] };

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let cp = |label: &str, src: &str, flags: &[&str]| -> Result<wgpu::ComputePipeline, SortError> {
            let code = preprocess(&format!("{COMMON_SRC}\n{src}"), flags)?;
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label:  Some(label),
                source: wgpu::ShaderSource::Wgsl(code.into()),
            });
            Ok(device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label:               Some(label),
                layout:              Some(&pipeline_layout),
                module:              &module,
                entry_point:         Some("main"),
                compilation_options: Default::default(),
                cache:               None,
            }))
        };

        let built = (|| {
            Ok::<_, SortError>((
                cp("wrdx counting", COUNT_SRC, &[])?,
                cp("wrdx prefix", PREFIX_SRC, prefix_flags)?,
                cp("wrdx scatter keys", SCATTER_SRC, ScatterVariant::KeysOnly.flags())?,
                cp("wrdx scatter key-values", SCATTER_SRC, ScatterVariant::KeyValues.flags())?,
            ))
        })();

        // The scope has to be popped even when preprocessing bailed out early.
        let scope = pollster::block_on(device.pop_error_scope());
        let (counting, prefix, scatter_keys, scatter_key_values) = built?;
        if let Some(err) = scope {
            return Err(SortError::KernelBuild(err.to_string()));
        }

        log::debug!("Radix sort kernels built (subgroups: {})", subgroups);

        Ok(Self {
            storage_layout,
            inout_layout,
            uniform_layout,
            counting,
            prefix,
            scatter_keys,
            scatter_key_values,
        })
    }

    /// Scatter pipeline of the given variant.
    pub fn scatter(&self, variant: ScatterVariant) -> &wgpu::ComputePipeline {
        match variant {
            ScatterVariant::KeysOnly  => &self.scatter_keys,
            ScatterVariant::KeyValues => &self.scatter_key_values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_preprocess_ifdef() {
        let src = "a\n#ifdef X\nb\n#else\nc\n#endif\nd\n";
        assert_eq!(preprocess(src, &["X"]).unwrap(), "a\nb\nd\n");
        assert_eq!(preprocess(src, &[]).unwrap(), "a\nc\nd\n");
    }

    #[test]
    fn test_preprocess_nested() {
        let src = "#ifndef X\n  #ifdef Y\ny\n  #else\nnot y\n  #endif\n#endif\nend\n";
        assert_eq!(preprocess(src, &["Y"]).unwrap(), "y\nend\n");
        assert_eq!(preprocess(src, &[]).unwrap(), "not y\nend\n");
        // an inactive outer block hides both inner branches
        assert_eq!(preprocess(src, &["X", "Y"]).unwrap(), "end\n");
        assert_eq!(preprocess(src, &["X"]).unwrap(), "end\n");
    }

    #[test]
    fn test_preprocess_unbalanced() {
        assert!(matches!(preprocess("#ifdef X\na\n", &[]), Err(SortError::KernelBuild(_))));
        assert!(matches!(preprocess("a\n#endif\n", &[]), Err(SortError::KernelBuild(_))));
        assert!(matches!(preprocess("#else\n", &[]), Err(SortError::KernelBuild(_))));
    }

    #[test]
    fn test_scatter_variants() {
        let keys = preprocess(SCATTER_SRC, ScatterVariant::KeysOnly.flags()).unwrap();
        let pairs = preprocess(SCATTER_SRC, ScatterVariant::KeyValues.flags()).unwrap();
        assert!(!keys.contains("dst_values"));
        assert!(pairs.contains("dst_values[dst] = src_values[tile_start + i];"));
        assert!(!pairs.contains('#'));
    }

    #[test]
    fn test_prefix_variants() {
        let plain = preprocess(PREFIX_SRC, &[]).unwrap();
        let sg = preprocess(PREFIX_SRC, &[SUBGROUPS_FLAG]).unwrap();
        assert!(!plain.contains("subgroupAdd"));
        assert!(plain.contains("stride >>= 1u"));
        assert!(sg.contains("subgroupAdd"));
        assert!(sg.contains("subgroup_invocation_id"));
        assert!(!sg.contains("stride >>= 1u"));
    }
}
