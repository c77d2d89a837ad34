/// Fixed interval between attempts.
pub mod fixed;
