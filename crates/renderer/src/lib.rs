//! Vector map rasterization and image encoding.
//!
//! - [`projection`]: linear world-to-pixel viewport
//! - [`canvas`] and [`scanline`]: RGBA buffer, coverage spans, scan conversion
//! - [`raster`]: per-geometry painting and layer ordering
//! - [`style`]: style resolution
//! - [`png`] and [`codec`]: PNG, JPEG and WebP output

pub mod canvas;
pub mod codec;
pub mod png;
pub mod projection;
pub mod raster;
pub mod scanline;
pub mod style;

pub use canvas::{Canvas, Coverage};
pub use codec::encode_image;
pub use png::{encode_png, save_png, EncodeError, PngOptions, PNG_SIGNATURE};
pub use projection::Viewport;
pub use map_common::LayerFeatures;
pub use raster::{render_map, CancelFlag, Rasterizer, RenderedMap};
pub use style::StyleResolver;
