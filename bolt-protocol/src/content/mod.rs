//! Content block codecs.
//!
//! `hessian` carries the SofaRequest / SofaResponse application types;
//! `protobuf` delegates message bodies to a caller supplied codec.

pub mod hessian;
pub mod protobuf;

pub use protobuf::{
    MethodDescriptor, MethodResolver, ProtobufCodec, ProtobufContext, SentRequest,
    SentRequestLookup, SentRequests,
};
