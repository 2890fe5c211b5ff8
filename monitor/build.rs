fn main() {
    // ESP-IDF link arguments and cfgs exported by esp-idf-sys.
    #[cfg(feature = "esp32")]
    embuild::espidf::sysenv::output();
}
