use std::process::ExitCode;

fn main() -> ExitCode {
    rebook_cli::run()
}
