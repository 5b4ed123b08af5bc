pub mod add;
pub mod grades;
pub mod review;
pub mod stats;
