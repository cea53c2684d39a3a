fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // Compile the Pulumi RPC schema (language runtime + resource monitor).
    // NOTE: type_attribute adds #[allow(missing_docs)] to all generated types
    // since protobuf-generated code cannot have doc comments at source
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(".", "#[allow(missing_docs)]")
        .compile(&["proto/pulumi.proto"], &["proto"])?;

    Ok(())
}
