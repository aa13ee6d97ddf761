mod clans;
mod locations;
mod players;
