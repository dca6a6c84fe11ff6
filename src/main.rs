fn main() {
    inflation_cert::cli::run();
}
