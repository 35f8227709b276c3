pub mod calib;
pub mod consts;
pub mod correct;
pub mod error;
pub mod frame;
pub mod io;
pub mod period;
pub mod pipeline;
pub mod quadrant;
pub mod science;
pub mod stack;
