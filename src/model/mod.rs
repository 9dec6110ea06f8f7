pub use attempt::*;
pub use content::*;
pub use ids::*;
pub use position::*;

mod attempt;
mod content;
mod ids;
mod position;
