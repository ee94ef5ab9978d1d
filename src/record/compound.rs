//! Statically declared record types.
//!
//! ```
//! hitree::compound! {
//!     pub struct Sample {
//!         pub id: u32,
//!         pub weights: [f32; 3],
//!     }
//! }
//!
//! use hitree::record::Compound;
//! assert_eq!(Sample::record_type().total_size(), 16);
//! ```
use super::{MemberType, RecordType};
use crate::types::Primitive;

/// A type that can be a member of a record.
pub trait Member: Sized {
    fn member_type() -> MemberType;

    /// Append the little-endian bytes to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Take the value from the front of `cur`, advancing it.
    fn decode(cur: &mut &[u8]) -> anyhow::Result<Self>;
}

/// A record type declared as a Rust struct, usually through [`compound!`](crate::compound).
pub trait Compound: Member + Default + Clone {
    fn record_type() -> RecordType;

    fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(Self::record_type().total_size());
        self.encode(&mut b);
        b
    }

    fn from_bytes(mut b: &[u8]) -> anyhow::Result<Self> {
        Self::decode(&mut b)
    }
}

macro_rules! impl_member {
    ($t:ty) => {
        impl Member for $t {
            fn member_type() -> MemberType {
                MemberType::Primitive(<$t as Primitive>::KIND)
            }

            fn encode(&self, out: &mut Vec<u8>) {
                let n = out.len();
                out.resize(n + std::mem::size_of::<$t>(), 0);
                <$t as Primitive>::encode(*self, &mut out[n..]);
            }

            fn decode(cur: &mut &[u8]) -> anyhow::Result<Self> {
                let n = std::mem::size_of::<$t>();
                ensure!(cur.len() >= n, "buffer too short for {}", stringify!($t));
                let v = <$t as Primitive>::decode(&cur[..n]);
                *cur = &cur[n..];
                Ok(v)
            }
        }
    };
}

impl_member!(u8);
impl_member!(u16);
impl_member!(u32);
impl_member!(u64);
impl_member!(i8);
impl_member!(i16);
impl_member!(i32);
impl_member!(i64);
impl_member!(f32);
impl_member!(f64);

impl<T: Member, const N: usize> Member for [T; N] {
    fn member_type() -> MemberType {
        MemberType::array(T::member_type(), N)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        for v in self {
            v.encode(out);
        }
    }

    fn decode(cur: &mut &[u8]) -> anyhow::Result<Self> {
        let v = (0..N)
            .map(|_| T::decode(cur))
            .collect::<anyhow::Result<Vec<T>>>()?;
        v.try_into()
            .map_err(|_| anyhow!("could not collect array of {}", N))
    }
}

/// Declare a struct as a record type.
///
/// Members are laid out in declaration order. Member types are primitives, other compounds, or fixed
/// arrays `[T; N]` of either.
#[macro_export]
macro_rules! compound {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($fvis:vis $field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        $vis struct $name {
            $($fvis $field: $ty),*
        }

        impl $crate::record::Member for $name {
            fn member_type() -> $crate::record::MemberType {
                $crate::record::MemberType::Record(
                    <$name as $crate::record::Compound>::record_type(),
                )
            }

            fn encode(&self, out: &mut ::std::vec::Vec<u8>) {
                $( $crate::record::Member::encode(&self.$field, out); )*
            }

            fn decode(cur: &mut &[u8]) -> $crate::Result<Self> {
                Ok($name {
                    $($field: <$ty as $crate::record::Member>::decode(cur)?),*
                })
            }
        }

        impl $crate::record::Compound for $name {
            fn record_type() -> $crate::record::RecordType {
                let mut t = $crate::record::RecordType::new();
                $( t.push_member(stringify!($field), <$ty as $crate::record::Member>::member_type()); )*
                t
            }
        }
    };
}
