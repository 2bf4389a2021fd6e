//! Buffers of the driver
//!
//! Memory on the receive and transmit paths is recycled instead of being freed after every
//! transfer.
//!
//! * Raw buffers of receive transfers come out of a [`Room`] and go back into it when the transfer
//!   cannot be resubmitted.
//! * Events and commands are held in [`SnetBuffer`]s, fetched from and parked back into a
//!   [`RecycleList`].
//! * ACL data is held in [`NetBuffer`]s that are created per frame and never pooled.
//!
//! Recycled buffers are not zeroed. Nothing should assume the bytes of a fetched or allocated
//! buffer are cleared.

mod net;
mod recycle;
mod room;
mod snet;

pub use net::NetBuffer;
pub use recycle::RecycleList;
pub use room::Room;
pub use snet::SnetBuffer;
