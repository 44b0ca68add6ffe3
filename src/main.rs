//! codescout binary entry point. All CLI logic is in the `cli` module.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    codescout::cli::run();
}
