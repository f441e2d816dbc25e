mod pending_uploads;
