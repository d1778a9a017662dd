fn main() {
    if let Err(err) = retail_analytics::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
