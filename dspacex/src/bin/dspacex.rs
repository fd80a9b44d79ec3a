fn main() {
    std::process::exit(
        match dspacex::cli::run_dspacex(std::env::args_os().collect::<Vec<_>>().as_slice()) {
            Ok(_) => 0,
            Err(_) => 1,
        },
    );
}
