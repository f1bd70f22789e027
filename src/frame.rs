use std::ops::Deref;

/// A received packet, borrowed straight out of its ring slot.
///
/// The view is only valid until the slot is handed back to the kernel, so it
/// never outlives the delivery call it is passed to.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
    ring: usize,
    slot: u32,
}

impl<'a> Frame<'a> {
    /// Create a new frame over a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            ring: 0,
            slot: 0,
        }
    }

    pub(crate) fn with_origin(mut self, ring: usize, slot: u32) -> Self {
        self.ring = ring;
        self.slot = slot;
        self
    }

    /// get the length of the frame
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// check if the frame is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// get the payload as a byte slice
    pub fn payload(&self) -> &'a [u8] {
        self.data
    }

    /// RX ring the frame was taken from.
    pub fn ring(&self) -> usize {
        self.ring
    }

    /// Slot index inside that ring.
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

impl<'a> Deref for Frame<'a> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl<'a> From<&'a [u8]> for Frame<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let data = b"test packet data";

        let frame = Frame::new(data);
        assert_eq!(frame.len(), data.len());
        assert_eq!(frame.payload(), data);
        assert!(!frame.is_empty());

        let frame: Frame = data.as_slice().into();
        assert_eq!(&frame[..4], b"test");
    }

    #[test]
    fn origin_is_recorded() {
        let frame = Frame::new(&[]).with_origin(2, 17);
        assert!(frame.is_empty());
        assert_eq!((frame.ring(), frame.slot()), (2, 17));
    }
}
