//! Protobuf message types for the OSM PBF container and primitive blocks,
//! generated by `build.rs` from `proto/*.proto`.

#![allow(clippy::all)]
#![allow(missing_docs)]

include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));
