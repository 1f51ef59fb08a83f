pub mod zhijiaoyun;
