fn main() {
    if let Err(error) = daylog::cli::run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
