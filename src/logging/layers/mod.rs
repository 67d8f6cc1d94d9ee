pub mod console;
pub mod file;

use tracing_subscriber::Layer;

/// Sinks are boxed so `init` can install whichever subset the config enables.
pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;
