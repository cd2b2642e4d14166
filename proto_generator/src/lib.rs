//! Nothing to see here. The work happens in `build.rs`, which writes the generated
//! protobuf code into `pointsink/src/proto`.
