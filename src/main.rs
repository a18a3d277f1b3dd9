use std::process::ExitCode;

use stackcopy::StackError;
use stackcopy::cli;

mod app;
mod logging;

fn main() -> ExitCode {
    let args = cli::parse();
    match app::run(args) {
        Ok(code) => code,
        Err(e) => {
            let code = e
                .downcast_ref::<StackError>()
                .map_or(1, StackError::code);
            stackcopy::output::print_error(&format!("{e:#}"));
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
