use std::env::var;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // List of proto files containing a message definition, relative to `proto_folder`
    let proto_files = &["echo.proto"];

    // Name of the folder containing the proto definitions
    let proto_folder = "proto";
    let out_dir = PathBuf::from(var("OUT_DIR").expect("Missing OUT_DIR environment variable"));

    // `protox` parses the protos in Rust, so building the crate does not require `protoc`
    let mut compiler = protox::Compiler::new([proto_folder])?;
    compiler.include_imports(true);
    compiler.open_files(proto_files)?;

    std::fs::write(
        out_dir.join("descriptors.bin"),
        compiler.encode_file_descriptor_set(),
    )?;

    tonic_prost_build::configure()
        .build_client(false)
        .compile_fds(compiler.file_descriptor_set())?;

    for file in proto_files {
        println!("cargo:rerun-if-changed={proto_folder}/{file}");
    }

    Ok(())
}
