//! HGFS error handling infrastructure.
//!
//! Provides the `define_hgfs_error!` macro so every error type in the client
//! core carries a subsystem code, a short description and the POSIX errno the
//! vnode layer hands back to the system call.
//!
//! ## Usage
//!
//! ### Simple errors
//! ```ignore
//! define_hgfs_error! {
//!     pub enum ChannelError(0x42) {
//!         Closed = 0x01 => "Channel closed" errno(5),
//!         Busy = 0x02 => "Channel busy" errno(16),
//!     }
//! }
//! ```
//!
//! ### Nested errors
//! A variant carrying an inner error takes its errno from the inner value, so
//! the inner type must implement [`Errno`].
//! ```ignore
//! define_hgfs_error! {
//!     pub enum MountError(0x43) {
//!         Channel(ChannelError) = 0x01 => "Transport failed",
//!     }
//! }
//! ```

#![no_std]

/// Conversion of an error value into a positive POSIX errno.
pub trait Errno {
    fn errno(&self) -> u32;
}

/// Macro to define an error type with consistent codes and errno mapping.
#[macro_export]
macro_rules! define_hgfs_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident($subsystem:literal) {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $(($inner:ty))? = $code:literal => $desc:literal $(errno($errno:expr))?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant $(($inner))?,
            )*
        }

        impl $name {
            /// Subsystem identifier for this error type.
            pub const SUBSYSTEM: u8 = $subsystem;

            /// Numeric error code, subsystem in the high byte.
            pub const fn code(&self) -> u16 {
                match self {
                    $(
                        $crate::define_hgfs_error!(@pattern $variant $(($inner))? _unused) => {
                            (($subsystem as u16) << 8) | $code
                        }
                    )*
                }
            }

            /// Short description for logging.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(
                        $crate::define_hgfs_error!(@pattern $variant $(($inner))? _unused) => {
                            $desc
                        }
                    )*
                }
            }
        }

        impl $crate::Errno for $name {
            fn errno(&self) -> u32 {
                match self {
                    $(
                        $crate::define_hgfs_error!(@pattern $variant $(($inner))? inner) => {
                            $crate::define_hgfs_error!(@errno_body ($($inner)?) ($($errno)?) inner)
                        }
                    )*
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self {
                    $(
                        $crate::define_hgfs_error!(@pattern $variant $(($inner))? inner) => {
                            $crate::define_hgfs_error!(@display_body self f $desc $(($inner))? inner)
                        }
                    )*
                }
            }
        }

        impl core::error::Error for $name {}
    };

    (@pattern $variant:ident ($inner:ty) $bind:ident) => { Self::$variant($bind) };
    (@pattern $variant:ident $bind:ident) => { Self::$variant };

    (@errno_body () ($errno:expr) $bind:ident) => { $errno };
    (@errno_body ($inner:ty) () $bind:ident) => { $crate::Errno::errno($bind) };

    (@display_body $self:ident $f:ident $desc:literal ($inner:ty) $bind:ident) => {
        write!($f, "E{:04X}: {} ({})", $self.code(), $desc, $bind)
    };
    (@display_body $self:ident $f:ident $desc:literal $bind:ident) => {
        write!($f, "E{:04X}: {}", $self.code(), $desc)
    };
}
