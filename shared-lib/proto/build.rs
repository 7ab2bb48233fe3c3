use std::env;
use std::path::PathBuf;

use prost::Message;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("echo_descriptor.bin");
    let protos = ["proto/echo/v1/echo.proto"];

    // Parse with protox so the build does not need a protoc binary
    let descriptors = protox::compile(protos, ["proto"])?;
    std::fs::write(&descriptor_path, descriptors.encode_to_vec())?;

    // Configure tonic-build
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(&descriptor_path)
        .skip_protoc_run()
        // JSON shape used by the HTTP gateway
        .type_attribute(
            ".echo.v1",
            "#[derive(serde::Serialize, serde::Deserialize)]\n#[serde(default)]",
        )
        .compile_protos(&protos, &["proto"])?;

    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
