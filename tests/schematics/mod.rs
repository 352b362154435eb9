mod consistency;
mod upgrade;
