//! Task handlers
//!
//! One [`TaskHandler`] per task kind, looked up through the
//! [`HandlerRegistry`] by the dispatcher.
//!
//! ## Key Components
//!
//! - [`TaskHandler`] - Trait every handler implements
//! - [`TaskContext`] - Payload, cancellation token and progress reporter for one run
//! - [`HandlerRegistry`] - Kind to handler mapping
//! - Built-in handlers for file batches and the gallery pipeline
//!
//! ## Example
//!
//! ```rust,ignore
//! use taskbox::handlers::{HandlerRegistry, PackImagesHandler};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(Arc::new(PackImagesHandler::new(enumerator, extensions)))?;
//! let handler = registry.get(TaskKind::PackImages)?;
//! let output = handler.execute(ctx).await?;
//! ```

mod archive;
mod convert_archive;
mod gallery;
mod pack_images;
mod registry;
mod shortcuts;
mod traits;
mod txt_to_epub;

pub(crate) use archive::blocking;
pub use convert_archive::Convert7zHandler;
pub use gallery::{GalleryCrawlHandler, GallerySearchHandler};
pub use pack_images::PackImagesHandler;
pub use registry::{HandlerRegistry, RegistryError};
pub use shortcuts::CreateShortcutsHandler;
pub use traits::{HandlerError, TaskContext, TaskHandler};
pub use txt_to_epub::TxtToEpubHandler;
