fn main() {
    // Exposes crate version, target and rustc details to `gruprune --version`
    built::write_built_file().expect("Failed to generate build info");
}
