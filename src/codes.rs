//! Symbol/code tables for instrument enumerations.
//!
//! Every enumerated instrument parameter has a symbolic name (used in settings
//! files, the CLI and logs) and an integer code (used on the wire). The
//! `coded_enum!` macro generates both directions of the mapping from a single
//! table so they cannot drift apart.

/// Declare an enum whose variants map one-to-one onto wire codes and symbols.
///
/// Generates `ALL`, `code()`, `symbol()`, `from_code()` (a miss is a
/// [`DaqError::Decode`](crate::error::DaqError::Decode)), `Display`, and a
/// case-insensitive `FromStr` (a miss is a
/// [`DaqError::Validation`](crate::error::DaqError::Validation)).
macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $field:literal {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $code:literal => $symbol:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $symbol)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in wire-code order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Integer code used on the wire.
            pub const fn code(self) -> i64 {
                match self {
                    $($name::$variant => $code,)+
                }
            }

            /// Symbolic name.
            pub const fn symbol(self) -> &'static str {
                match self {
                    $($name::$variant => $symbol,)+
                }
            }

            /// Look up the variant for a code returned by the instrument.
            pub fn from_code(code: i64) -> $crate::error::AppResult<Self> {
                match code {
                    $($code => Ok($name::$variant),)+
                    _ => Err($crate::error::DaqError::Decode { field: $field, code }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.symbol())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::DaqError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.symbol().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        let known: Vec<&str> = $name::ALL.iter().map(|v| v.symbol()).collect();
                        $crate::error::DaqError::Validation(format!(
                            "unknown {} '{}' (expected one of: {})",
                            $field,
                            wanted,
                            known.join(", ")
                        ))
                    })
            }
        }
    };
}

pub(crate) use coded_enum;
