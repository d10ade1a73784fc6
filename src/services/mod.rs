pub mod cache;
pub mod forecast;
pub mod history;
pub mod location_mapper;
pub mod locations;
pub mod onecall;
pub mod openweathermap;
pub mod provider;
pub mod scheduler;
pub mod settings;
pub mod timeseries;
pub mod weather;
