// Trait to generalize over primitive number types usable as raw receive buffers.
pub trait Align1: bytemuck::Pod {}

impl Align1 for u8 {}
impl Align1 for u32 {}
impl Align1 for u64 {}
impl Align1 for f32 {}
impl Align1 for f64 {}

// Trait to generalize over primitive number types that are at least 4 bytes aligned,
// these are the only buffers an `f32` payload can be viewed through without copying.
pub trait Align4: Align1 {}

impl Align4 for u32 {}
impl Align4 for u64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}
