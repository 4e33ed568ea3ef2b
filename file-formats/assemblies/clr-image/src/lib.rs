//! # clr_image - Managed Assembly Image Reader
//!
//! Reads the declared identity and the assembly references of a managed
//! (CLI) portable executable without loading the whole file.
//!
//! ## Features
//!
//! - PE32 and PE32+ headers, RVA to file offset mapping
//! - CLI header, metadata root and stream headers
//! - Row layout for every ECMA-335 table up to GenericParamConstraint
//! - Deferred reads of the Assembly and AssemblyRef rows
//! - Read limits for untrusted input
//! - A builder for minimal identity-only images
//!
//! ## Examples
//!
//! ```no_run
//! use clr_image::AssemblyImage;
//!
//! # fn main() -> Result<(), clr_image::Error> {
//! let mut image = AssemblyImage::open("BepInEx/core/MonoMod.Utils.dll")?;
//! let identity = image.identity()?;
//! println!("{identity}");
//!
//! for reference in image.references()? {
//!     println!("  -> {}", reference.name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ```
//! use clr_image::{AssemblyImage, ImageBuilder, Version};
//!
//! # fn main() -> Result<(), clr_image::Error> {
//! let data = ImageBuilder::new("Stub").version(Version::new(2, 1, 0, 0)).build()?;
//! let mut image = AssemblyImage::from_bytes(data)?;
//! assert_eq!(image.name()?, "Stub");
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod builder;
pub mod error;
pub mod identity;
pub mod image;
pub mod limits;
pub mod metadata;
pub mod pe;
pub mod tables;

pub use builder::{ImageBuilder, ImageKind};
pub use error::{Error, Result};
pub use identity::{AssemblyIdentity, AssemblyReference, Version};
pub use image::AssemblyImage;
pub use limits::ReadLimits;
pub use metadata::{CliHeader, MetadataRoot, StreamHeader};
pub use pe::{PeHeaders, SectionHeader};
pub use tables::TablesHeader;
