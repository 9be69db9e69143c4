pub mod pod;

pub use pod::render_runner_pod;
