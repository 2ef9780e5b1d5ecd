use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match hospital_api::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hospital-api: {e}");
            ExitCode::FAILURE
        }
    }
}
