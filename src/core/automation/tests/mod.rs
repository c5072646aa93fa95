mod driver;
mod gate;
mod organization;
mod state_machine;
mod trigger;
