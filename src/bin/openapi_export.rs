use std::{fs, path::PathBuf};

use marketplace_payments::openapi::ApiDocV1;
use utoipa::OpenApi;

/// Writes the v1 OpenAPI document next to the crate for client generation.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&ApiDocV1::openapi())?;

    let output_dir = PathBuf::from("openapi");
    fs::create_dir_all(&output_dir)?;

    let output_path = output_dir.join("marketplace-payments.v1.json");
    fs::write(&output_path, json)?;

    println!("OpenAPI document written to {}", output_path.display());
    Ok(())
}
