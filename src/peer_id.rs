use std::fmt::Debug;
use std::hash::Hash;

/// Identifies a peer (device). Advertisements carry ids as `u32` on the wire, and the
///  transport is generic over the application's id type as long as it can be converted from
///  that representation.
///
/// Ids that are not representable in the application's id type (e.g. an advertised id of 300
///  for a `u8` id) are dropped when the advertisement is received.
pub trait PeerId: Copy + Eq + Ord + Hash + Debug + Send + 'static {
    fn from_wire(raw: u32) -> Option<Self>;
}

impl <T> PeerId for T
where T: TryFrom<u32> + Copy + Eq + Ord + Hash + Debug + Send + 'static
{
    fn from_wire(raw: u32) -> Option<Self> {
        T::try_from(raw).ok()
    }
}
