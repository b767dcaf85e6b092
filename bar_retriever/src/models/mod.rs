pub mod bar;
pub mod bar_series;
pub mod bar_size;
pub mod request_params;
