pub mod chunk;
pub mod flash_detector;
pub mod grid_manager;
pub mod pixel;
pub mod risk_window;
pub mod verdict;
