fn main() {
    println!("cargo:rerun-if-changed=./dash.proto");
    tonic_build::compile_protos("./dash.proto")
        .unwrap_or_else(|err| panic!("Failed to compile protos {:?}", err));
}
