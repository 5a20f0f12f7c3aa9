/// Types that can be written into the body of a frame.
pub trait Serialize<'a> {
    /// Writes the owned part of the body into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, already holding the length prefix.
    ///
    /// # Returns
    /// A borrowed tail to be written right after `buf` without copying, if any.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
