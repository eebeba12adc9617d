//! HTTP method enum, built with the teacher's `define_it!` macro
//! (`crates/httpserver/src/serve/common/method.rs`), extended with the
//! verbs `original_source/seal-server.py` recognizes:
//! `GET, HEAD, POST, PUT, DELETE, CONNECT, TRACE, OPTIONS`. Parsing never
//! fails; unknown verbs fall into `Other`, matching the macro's
//! permissive `FromStr`. The Handler's dispatch rejects `Other` with
//! `BadMethod` (spec §5.5 step 3), since the proxy itself only speaks the
//! eight known verbs.

use pastey::paste;

#[macro_export]
macro_rules! define_method_enum {
    (
        $(#[$attr_meta:meta])*
        $v:vis enum $name:ident {
            $(#[$other_attr_meta:meta])*
            $other:ident($inner:ty),
            $(
                $(#[$ident_attr_meta:meta])*
                $idents:ident
            ),* $(,)?
        }
    ) => {
        $(#[$attr_meta])*
        $v enum $name {
            $(#[$other_attr_meta])*
            $other($inner),
            $(
                $(#[$ident_attr_meta])*
                $idents,
            )*
        }

        impl $name {
            pub const ITEMS: &'static [Self] = &[
                $(Self::$idents,)*
            ];
        }

        paste! {
            impl $name {
                $(
                    #[inline]
                    pub fn [<$idents:lower>]() -> Self {
                        Self::$idents
                    }
                )*
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                match self {
                    Self::$other(v) => write!(f, "{v}"),
                    $( Self::$idents => write!(f, "{}", stringify!($idents).to_ascii_uppercase()), )*
                }
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = ::core::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                match () {
                    $(
                        _ if trimmed.eq_ignore_ascii_case(stringify!($idents)) => Ok(Self::$idents),
                    )*
                    _ => Ok(Self::$other(trimmed.to_string())),
                }
            }
        }
    };
}

define_method_enum!(
    #[derive(Eq, Hash, PartialEq, Debug, Clone)]
    pub enum Method {
        Other(String),
        Get,
        Head,
        Post,
        Put,
        Delete,
        Connect,
        Trace,
        Options,
    }
);

impl Method {
    /// `true` for the verbs the spec declares body-less regardless of
    /// framing headers: `GET/HEAD/DELETE/CONNECT/TRACE`.
    pub fn is_always_bodyless(&self) -> bool {
        matches!(
            self,
            Method::Get | Method::Head | Method::Delete | Method::Connect | Method::Trace
        )
    }

    /// `true` for the eight verbs this proxy knows how to dispatch;
    /// anything else (`Other`) is rejected with `BadMethod`.
    pub fn is_known(&self) -> bool {
        !matches!(self, Method::Other(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_known_verbs_case_insensitively() {
        assert_eq!(Method::from_str("get").unwrap(), Method::Get);
        assert_eq!(Method::from_str("CONNECT").unwrap(), Method::Connect);
    }

    #[test]
    fn unknown_verb_becomes_other() {
        assert_eq!(
            Method::from_str("PATCH").unwrap(),
            Method::Other("PATCH".to_string())
        );
        assert!(!Method::Other("PATCH".to_string()).is_known());
    }

    #[test]
    fn bodyless_methods() {
        assert!(Method::Get.is_always_bodyless());
        assert!(Method::Connect.is_always_bodyless());
        assert!(!Method::Post.is_always_bodyless());
        assert!(!Method::Put.is_always_bodyless());
    }

    #[test]
    fn display_round_trips_to_upper() {
        assert_eq!(Method::Post.to_string(), "POST");
    }
}
