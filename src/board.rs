/// Hardware abstraction for supported boards.
///
/// Each board module defines pin assignments and capabilities
/// selected at compile time via feature flags.

#[cfg(feature = "board-devkit")]
mod hw {
    pub const BUTTON_PIN: u8 = 0; // BOOT button, active low
    pub const LED_PIN: u8 = 2;
    pub const LED_ACTIVE_HIGH: bool = true;
    pub const BOARD_NAME: &str = "esp32_devkit";
}

#[cfg(feature = "board-xiao")]
mod hw {
    pub const BUTTON_PIN: u8 = 0; // BOOT button, active low
    pub const LED_PIN: u8 = 21; // User LED
    pub const LED_ACTIVE_HIGH: bool = false;
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(not(any(feature = "board-devkit", feature = "board-xiao")))]
mod hw {
    pub const BUTTON_PIN: u8 = 0;
    pub const LED_PIN: u8 = 2;
    pub const LED_ACTIVE_HIGH: bool = true;
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;

/// Button sampling period shared by the button and watchdog threads.
pub const TICK_MS: u32 = 10;
