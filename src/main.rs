fn main() {
    if let Err(err) = bulk_populate::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
