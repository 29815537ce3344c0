//! `argonc` entry point.

fn main() {
    std::process::exit(argon::cli::run_cli());
}
