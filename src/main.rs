use barrow::cli;
use barrow::storage::{password::PasswordStore, pool::ServerPool};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = cli::run(&args);

    // Tear down process-wide state before exiting.
    PasswordStore::instance().shutdown();
    ServerPool::instance().shutdown();
    std::process::exit(code);
}
