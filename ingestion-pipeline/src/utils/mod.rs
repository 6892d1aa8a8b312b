pub mod image_captioning;
