pub mod entity;
pub mod evidence;
pub mod knowledge;
pub mod normalize;
pub mod pii;
