pub mod stm32_gpio;
pub mod sysctl;
pub mod tm4c_gpio;

pub use stm32_gpio::Stm32Gpio;
pub use sysctl::SysCtl;
pub use tm4c_gpio::Tm4cGpio;
