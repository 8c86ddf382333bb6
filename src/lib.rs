pub mod config;
pub mod control;
pub mod hardware;
pub mod kinematics;
pub mod messages;
pub mod odometry;
pub mod runtime;
pub mod sensors;
