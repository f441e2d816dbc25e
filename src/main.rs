fn main() {
    if let Err(err) = punchcam_lib::run() {
        eprintln!("punchcam failed: {err:#}");
        std::process::exit(1);
    }
}
