//! Generic leaf blocks
//!
//! Small building blocks over any [`Item`](crate::runtime::ports::Item) type:
//! - **Sources**: [`VectorSource`]
//! - **Sinks**: [`VectorSink`], [`NullSink`]
//! - **Pass-through**: [`CopyBlock`], [`Head`]
//! - **Rate changers**: [`KeepOneInN`] (decimating), [`Repeat`] (interpolating)

mod copy;
mod head;
mod keep_one_in_n;
mod null_sink;
mod repeat;
mod vector_sink;
mod vector_source;

pub use copy::CopyBlock;
pub use head::Head;
pub use keep_one_in_n::KeepOneInN;
pub use null_sink::NullSink;
pub use repeat::Repeat;
pub use vector_sink::VectorSink;
pub use vector_source::VectorSource;
