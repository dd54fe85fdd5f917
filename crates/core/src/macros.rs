// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative macros for reducing boilerplate.
//!
//! - [`define_id!`] — newtype ID wrapper over `SmolStr` with a type prefix
//! - [`simple_display!`] — `Display` impl mapping enum variants to string literals
//! - [`setters!`] — chained `impl Into` setters for config structs

/// Define a newtype ID wrapper around [`smol_str::SmolStr`] with a type prefix.
///
/// Generates `generate()` for random ID creation, `new()` for wrapping an
/// existing name, `as_str()`, `Display`, `From<&str>`/`From<String>`,
/// `AsRef<str>`, `Borrow<str>`, and `PartialEq<str>` implementations.
///
/// Generated IDs are `{prefix}{nanoid}` where the prefix is a short type
/// indicator (e.g. `"job-"`, `"act-"`) and the nanoid is 12 random chars.
/// Most IDs in a simulation are user-chosen names wrapped via `new()`.
///
/// ```ignore
/// define_id! {
///     /// Doc comment for the ID type.
///     pub struct JobId("job-");
/// }
/// ```
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(smol_str::SmolStr);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random ID with the type prefix.
            pub fn generate() -> Self {
                Self(smol_str::SmolStr::new(format!(
                    "{}{}",
                    $prefix,
                    nanoid::nanoid!(12)
                )))
            }

            /// Wrap an existing name or parsed ID.
            pub fn new(id: impl AsRef<str>) -> Self {
                Self(smol_str::SmolStr::new(id.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.0.as_str())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0.as_str() == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0.as_str() == *other
            }
        }
    };
}

/// Generate a `Display` impl that maps enum variants to string literals.
///
/// Unit variants match directly; data-carrying variants use `(..)` or
/// `{ .. }` to ignore fields.
///
/// ```ignore
/// crate::simple_display! {
///     MyEnum {
///         Foo => "foo",
///         Bar(..) => "bar",
///     }
/// }
/// ```
#[macro_export]
macro_rules! simple_display {
    ($enum:ty { $( $variant:ident $(( $($pignore:tt)* ))? $({ $($bignore:tt)* })? => $str:expr ),+ $(,)? }) => {
        impl std::fmt::Display for $enum {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $( Self::$variant $(( $($pignore)* ))? $({ $($bignore)* })? => $str, )+
                })
            }
        }
    };
}

/// Generate chained setter methods inside an existing `impl` block.
///
/// One setter per `field: Type` line, each taking `impl Into<Type>`
/// (identity for plain values). Doc attributes on a line carry over to
/// its setter.
///
/// ```ignore
/// impl MyConfig {
///     gantry_core::setters! {
///         /// Declared work quantity.
///         flops: f64,
///         name: String,
///     }
/// }
/// ```
#[macro_export]
macro_rules! setters {
    ( $( $(#[$meta:meta])* $field:ident : $ty:ty ),+ $(,)? ) => {
        $(
            $(#[$meta])*
            pub fn $field(mut self, v: impl Into<$ty>) -> Self {
                self.$field = v.into();
                self
            }
        )+
    };
}
