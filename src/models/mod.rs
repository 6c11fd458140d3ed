pub mod category;
pub mod interaction;
pub mod item;
pub mod preferences;
pub mod recommendation;
pub mod settings;
pub mod storage;

pub use category::*;
pub use interaction::*;
pub use item::*;
pub use preferences::*;
pub use recommendation::*;
pub use settings::*;
pub use storage::*;
