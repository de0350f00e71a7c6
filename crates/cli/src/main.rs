use std::process::ExitCode;

fn main() -> ExitCode {
    routeslip_cli::run()
}
