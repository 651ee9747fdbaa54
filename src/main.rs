fn main() {
    wrdx::main();
}
