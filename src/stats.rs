//! Statistics of a device
//!
//! The counters are updated from transfer completions without taking any lock, so a snapshot taken
//! while transfers complete may be slightly inconsistent between counters.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! statistics {
    ( $( $(#[$doc:meta])* $name:ident ),* $(,)? ) => {
        /// Counters of a device
        #[derive(Debug, Default)]
        pub struct Statistics {
            $( $(#[$doc])* pub(crate) $name: AtomicU64, )*
        }

        /// A copy of the counters of a device
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct HciStatistics {
            $( $(#[$doc])* pub $name: u64, )*
        }

        impl Statistics {
            /// Take a snapshot of the counters
            pub fn snapshot(&self) -> HciStatistics {
                HciStatistics {
                    $( $name: self.$name.load(Ordering::Relaxed), )*
                }
            }

            /// Zero every counter
            pub fn clear(&self) {
                $( self.$name.store(0, Ordering::Relaxed); )*
            }
        }
    };
}

statistics! {
    /// Transmit transfers accepted by the USB bus
    accepted_tx,
    /// Transmit transfers the USB bus refused to queue
    rejected_tx,
    /// Transmit transfers that completed successfully
    successful_tx,
    /// Transmit transfers that completed with an error
    error_tx,
    /// Receive transfers accepted by the USB bus
    accepted_rx,
    /// Receive transfers the USB bus refused to queue
    rejected_rx,
    /// Receive transfers whose data was assembled
    successful_rx,
    /// Receive transfers whose data could not be assembled
    error_rx,
    command_tx,
    event_rx,
    acl_tx,
    acl_rx,
    sco_tx,
    bytes_rx,
    bytes_tx,
}

impl Statistics {
    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(amount as u64, Ordering::Relaxed);
    }
}
