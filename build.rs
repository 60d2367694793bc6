fn main() {
    // PBF wire schema, generated with the pure-Rust parser so no protoc is needed
    protobuf_codegen::Codegen::new()
        .pure()
        .includes(["proto"])
        .input("proto/fileformat.proto")
        .input("proto/osmformat.proto")
        .cargo_out_dir("protos")
        .run_from_script();

    println!("cargo:rerun-if-changed=proto/");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
