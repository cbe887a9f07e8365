use flotilla::cli::{report_error, Cli};

fn main() {
    match Cli::run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            report_error(&e);
            std::process::exit(1);
        }
    }
}
