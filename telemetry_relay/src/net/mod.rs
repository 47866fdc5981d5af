pub mod framing;
pub mod link;
pub mod tcp;
