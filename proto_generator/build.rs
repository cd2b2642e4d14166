use std::path::PathBuf;
#[allow(clippy::unwrap_used)]
fn main() {
    let out_dir = PathBuf::from("../pointsink/src/proto");
    let proto_dir = "../proto";

    eprintln!("Hi brave developer! If you are changing protos and pointsink fails to build, please retry 1 time.");
    eprintln!("Cargo currently does not have a nice way for me to express a dependency order between these 2");
    eprintln!("workspace projects - because this project is _specifically_ supposed to not be a Cargo dependency.");
    eprintln!("I did this so users don't need to have protoc when compiling pointsink!");

    tonic_build::configure()
        .build_client(false)
        .build_server(false)
        .out_dir(out_dir.clone())
        .compile_protos(&[format!("{proto_dir}/prometheus/remote.proto")], &[proto_dir])
        .unwrap();

    tonic_build::configure()
        .build_server(false)
        .type_attribute("ExportTracePartialSuccess", "#[derive(Eq)]")
        .type_attribute("ExportTraceServiceResponse", "#[derive(Eq)]")
        .out_dir(out_dir)
        .compile_protos(
            &[
                format!("{proto_dir}/opentelemetry/proto/trace/v1/trace.proto"),
                format!("{proto_dir}/opentelemetry/proto/collector/trace/v1/trace_service.proto"),
                format!("{proto_dir}/opentelemetry/proto/common/v1/common.proto"),
                format!("{proto_dir}/opentelemetry/proto/resource/v1/resource.proto"),
            ],
            &[proto_dir],
        )
        .unwrap();

    println!("cargo:rerun-if-changed=../proto");
}
