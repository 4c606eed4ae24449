mod hrt;
