use std::path::PathBuf;

#[tokio::main]
async fn main() {
    mailsort::init_tracing();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    if let Err(e) = mailsort::run(config_path).await {
        tracing::error!(error = %e, "mailsort exited with an error");
        eprintln!("mailsort: {}", e);
        std::process::exit(1);
    }
}
