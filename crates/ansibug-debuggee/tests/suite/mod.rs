mod breakpoints;
mod lifecycle;
mod requests;
mod shutdown;
