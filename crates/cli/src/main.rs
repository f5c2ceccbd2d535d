use std::process::ExitCode;

fn main() -> ExitCode {
    pricepoint_cli::run()
}
