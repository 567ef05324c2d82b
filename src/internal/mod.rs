pub mod broadcaster;
pub mod codec;
pub mod connection;
pub mod data_types;
pub mod error;
pub mod events;
pub mod loopback;
pub mod media;
pub mod registry;
pub mod rendezvous;
pub mod simple_webrtc;
pub mod transport;
